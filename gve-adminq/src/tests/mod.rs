mod negotiate;

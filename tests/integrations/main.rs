mod test_gateway;
